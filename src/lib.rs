// Modules
pub mod config;
pub mod crossfit;
pub mod data;
pub mod errors;
pub mod estimator;
pub mod learner;
pub mod metric;
pub mod nodes;
pub mod nuisance;
pub mod objective;
pub mod prepare;
pub mod shift;
pub mod utils;

// Individual classes, and functions
pub use config::{MtpConfig, OutcomeType, TreatmentType, Trim, Variables};
pub use data::{Frame, Matrix};
pub use errors::{MtpError, NumericWarning};
pub use estimator::{Estimator, MtpEstimator, MtpResult};
pub use learner::{Learner, SuperLearner};
pub use shift::Policy;
