pub mod actionness;
pub mod bbox;
pub mod beam_linker;
pub mod dynamic_linker;
pub mod enumerator;
pub mod overlay;
pub mod proposal;
pub mod scorer;
pub mod toi_pool;
