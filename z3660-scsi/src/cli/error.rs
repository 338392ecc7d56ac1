use std::io;

#[derive(Debug)]
pub struct CliError(pub String);

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError(format!("Failed to write output: {}", e))
    }
}
