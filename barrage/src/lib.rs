#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod collector;
pub mod dispatcher;
pub mod http;
pub mod pool;
pub mod run;
pub mod sample;
pub mod scenario;
pub mod threshold;
pub mod transaction;

pub(crate) mod measurement;
pub(crate) mod ticker;
pub(crate) mod worker;

pub use barrage_core as core;
pub use run::{RunState, Runner};

pub mod prelude {
    pub use crate::collector::MetricsCollector;
    pub use crate::http::{HttpClient, HttpProbe, ReqwestClient};
    pub use crate::run::{RunState, Runner};
    pub use crate::sample::{ErrorTag, Outcome};
    pub use crate::scenario::{exec_fn, Exec, ExecContext, ExecError, ExecRegistry};
    pub use crate::transaction::{check, transaction};

    pub use barrage_core::{
        ConfigError, HttpProbeConfig, RunConfig, RunReport, ScenarioConfig, Stage, ThresholdSpec,
    };
}
