pub mod aligner;
pub mod alignments;
pub mod output;
pub mod tables;
