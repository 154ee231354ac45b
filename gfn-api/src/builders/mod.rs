pub mod estimators;
pub mod gflownet;
pub mod mlp;
pub mod optimizer;
