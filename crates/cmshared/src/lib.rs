//! Shared types for the Carme gateway: the Jupyter wire envelope, the backend's
//! kernel and session descriptors, and the outward execution result shape.

pub mod execution_result;
pub mod jupyter_message;
pub mod kernel_info;
