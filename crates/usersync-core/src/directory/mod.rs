// # Directory Implementations
//
// In-process DirectoryClient implementations. Provider bindings live in their
// own crates (see `usersync-directory-cognito`).

pub mod memory;

pub use memory::{MemoryDirectory, MemoryDirectoryFactory};
