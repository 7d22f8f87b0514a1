pub mod remat;

pub use remat::{Anomaly, AnomalyPolicy, FailFast, MAX_LEGIT_CHANGES, Record, RematDetector};
