pub mod memory;
pub mod rest_backend;
pub mod traits;

pub use memory::InMemoryRoutineStore;
pub use rest_backend::SupabaseRoutineStore;
pub use traits::{NewRoutine, NewRun, RoutinePatch, RoutineStore};
