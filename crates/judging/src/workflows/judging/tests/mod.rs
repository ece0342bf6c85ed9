mod common;
mod conflicts;
mod pipeline;
