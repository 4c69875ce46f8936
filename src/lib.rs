pub mod collision;
pub mod ensemble;
pub mod error;
pub mod gate;
pub mod geom;
pub mod output;
pub mod packing;
pub mod proposer;
pub mod settings;
