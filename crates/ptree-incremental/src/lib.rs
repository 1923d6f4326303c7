pub mod journal;

pub use journal::{ChangeEvent, ChangeFileInfo, ChangeJournal, ChangeKind};
