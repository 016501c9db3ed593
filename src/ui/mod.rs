pub mod icons;
pub mod progress;
pub mod report;

pub use progress::DeployUI;
pub use report::render_result;
