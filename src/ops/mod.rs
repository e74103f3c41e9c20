pub mod compose;
pub mod depth;
pub mod refine;
pub mod text;
