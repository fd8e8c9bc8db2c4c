mod gate;

pub use gate::StartGate;
