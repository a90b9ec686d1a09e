mod flat;
mod normalize;
mod persist;
