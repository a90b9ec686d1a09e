mod benchmark;
mod kernel;
mod sim;
