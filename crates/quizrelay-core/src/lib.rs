#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
pub use common::types::{Channel, ClientIdentity, CommittedPosition, Family, SequenceMarker};
pub use common::wire::{ExplanationWork, QuestionWork, Workload};
