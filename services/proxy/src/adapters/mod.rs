pub mod booklore;
pub mod db;

pub use booklore::{BookloreClient, UpstreamError, UpstreamResponse};
pub use db::MySqlAdapter;
