pub mod wire;

pub use wire::{build_query, parse_response, EdnsOpts, LwResult, Name, ParseError, Question, QueryOpts, RData, ResourceRecord};
