pub mod mirror;

pub use mirror::{CloudSync, DataKind, RemoteMirror};
