// External collaborator adapters.

pub mod auth;
