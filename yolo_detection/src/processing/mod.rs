pub mod post;
pub mod pre;

pub use post::PostProcessor;
pub use pre::letterbox;
