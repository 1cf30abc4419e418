use anyhow::Result;
use converge::{Fingerprint, Operation};

pub fn run(operation: &str, unit: &str) -> Result<()> {
    let operation: Operation = operation.parse()?;
    println!("{}", Fingerprint::of(operation, unit));
    Ok(())
}
