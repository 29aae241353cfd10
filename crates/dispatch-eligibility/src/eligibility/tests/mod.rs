mod common;
mod pipeline;
mod registry;
mod service;
