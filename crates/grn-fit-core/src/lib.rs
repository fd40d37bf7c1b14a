pub mod cmaes;
pub mod config;
pub mod constants;
pub mod controller;
pub mod encoding;
pub mod events;
pub mod genes;
pub mod linalg;
pub mod network;
pub mod objective;
pub mod params;
pub mod rng;
pub mod simulator;

pub use cmaes::{CmaEs, CmaEsError};
pub use config::{RunConfig, RunConfigError, TimeCourseTarget};
pub use constants::{LINEAGE_COUNT, MAX_EXPRESSION};
pub use controller::{ControllerError, Optimization, RunControl, RunHandle};
pub use encoding::{EncodingConfig, ParameterCodec};
pub use events::{DoneEvent, ProgressEvent, RunEvent, RunSummary};
pub use genes::GeneGroups;
pub use network::GrnTopology;
pub use objective::{Phase, TargetState};
pub use params::{GlobalParams, ParamsBlob, ParamsBlobError, SimulationParams};
pub use simulator::{CellState, GrnSimulator, SimulationOptions, StabilityReport};
