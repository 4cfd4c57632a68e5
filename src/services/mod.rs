pub mod aggregator;
pub mod captcha;
pub mod catalog;
pub mod classifier;
pub mod dispatcher;
pub mod form;
pub mod queue;
pub mod rate_limit;
pub mod recorder;
pub mod validation;
pub mod worker;
