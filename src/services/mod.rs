pub mod digitizer;
pub mod production_pack;
pub mod queue;
