//! Bakes the build time and git state into `bragi::version`.

use vergen_gitcl::{Build, Emitter, Gitcl};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut emitter = Emitter::default();
    emitter.add_instructions(&Build::builder().build_timestamp(true).build())?;
    emitter.add_instructions(&Gitcl::builder().branch(true).sha(true).dirty(true).build())?;
    emitter.emit()?;
    Ok(())
}
