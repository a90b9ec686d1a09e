mod strategy;
mod tracer;
