pub mod column;
pub mod datatype;
pub mod state;
