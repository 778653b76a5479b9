pub mod delete_document;
pub mod delete_index;
pub mod extract;
pub mod gen_embeddings;
pub mod partition;
pub mod save_embeddings;
pub mod summarize;
