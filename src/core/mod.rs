pub mod agent;
pub mod brain;
pub mod delegation;
pub mod lifecycle;
pub mod llm;
pub mod runtime;
pub mod scheduler;
pub mod supervisor;
pub mod terminal;
pub mod tools;
pub mod triggers;

#[cfg(test)]
pub(crate) mod test_support;
