pub mod velocity_anomaly;

pub use velocity_anomaly::VelocityAnomalyDetector;
