//! Outbound results streaming: one supervised task per streamed event.

mod supervisor;
mod task;

pub use supervisor::{Collaborators, StreamingSupervisor};
