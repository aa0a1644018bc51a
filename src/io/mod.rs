pub mod disk;
pub mod loader;

pub use disk::Disk;

/// Anything programs can be admitted from.
pub trait ProgramSource {
    /// Source lines of the named program, or `None` when it does not exist.
    fn read_program(&self, name: &str) -> Option<Vec<String>>;
}
