// Adapters layer: clients for external systems (GitHub, Polar, Git, PyPI) and the index server.

pub mod git;
pub mod github;
pub mod http;
pub mod index_server;
pub mod polar;
pub mod pypi;
