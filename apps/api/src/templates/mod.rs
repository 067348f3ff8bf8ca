// Template packaging: manifest contract, archive installer, JSON registry and
// the relational catalog that mirrors installs for the admin listing.
// Uploaded template code is stored and served statically, never executed here.

pub mod catalog;
pub mod handlers;
pub mod installer;
pub mod manifest;
pub mod registry;

#[cfg(test)]
pub mod test_support;
