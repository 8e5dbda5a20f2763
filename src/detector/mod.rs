//! Detector module: capability resolution over compiled rules
pub mod resolver;
pub mod detector;

pub use self::resolver::{CapabilityResolver, NoHooks, ResolverHooks};
pub use self::detector::BrowserCapsDetector;
