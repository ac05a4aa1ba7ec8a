
mod unit;
