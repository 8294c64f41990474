pub mod position_processor;
