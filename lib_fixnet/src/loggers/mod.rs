/// Console and file logging setup built on `fern`.
pub mod logfile;
