// Pipeline processing: normalization stages and export sinks

pub mod export;
pub mod normalize;
