//! Run configuration resolver: descriptor parsing, the descriptor/argv codec,
//! log replay, command planning and descriptor registration.

pub mod codec;
pub mod descriptor;
pub mod log_replay;
pub mod plan;
pub mod registration;
pub mod vocabulary;

pub use codec::{command_line, decode_args, encode_args, tokenize};
pub use descriptor::{descriptor_stem, is_descriptor_path, Descriptor, ParamValue};
pub use log_replay::{descriptor_from_log, read_command_line, write_descriptor};
pub use plan::{job_type_for, plan, CandidateFile, PlanInput, ResolvedCommand};
pub use registration::{ingest_descriptor, RegistrationOutcome};
pub use vocabulary::{ParamKind, VOCABULARY};
