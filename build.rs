//! Build script rendering the `garm-provider-openstack(1)` manual page.
//!
//! Besides the clap-derived options, the page documents the `GARM_COMMAND`
//! vocabulary and the exit statuses the runner-pool manager interprets.

use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
#[expect(dead_code, reason = "the build script only renders the parser")]
mod cli;

use cli::{COMMAND_NAMES, Cli};

const MAN_PAGE: &str = "garm-provider-openstack.1";

const EXIT_STATUSES: [(&str, &str); 4] = [
    ("0", "The command succeeded."),
    ("1", "The command failed; the reason is written to standard error."),
    ("30", "No instance owned by this controller matched."),
    ("31", "More than one instance matched a name; manual intervention is required."),
];

fn render_commands(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, ".SH COMMANDS")?;
    writeln!(
        out,
        "The operation is read from GARM_COMMAND. CreateInstance reads its bootstrap request as JSON on standard input."
    )?;
    for name in COMMAND_NAMES {
        writeln!(out, ".TP\n\\fB{name}\\fR")?;
    }
    Ok(())
}

fn render_exit_statuses(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, ".SH \"EXIT STATUS\"")?;
    for (code, meaning) in EXIT_STATUSES {
        writeln!(out, ".TP\n\\fB{code}\\fR\n{meaning}")?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let man = Man::new(Cli::command()).manual("GARM external providers");
    let mut page = Vec::new();
    man.render_title(&mut page)?;
    man.render_name_section(&mut page)?;
    man.render_synopsis_section(&mut page)?;
    man.render_description_section(&mut page)?;
    man.render_options_section(&mut page)?;
    render_commands(&mut page)?;
    render_exit_statuses(&mut page)?;
    man.render_extra_section(&mut page)?;
    man.render_version_section(&mut page)?;

    File::create(out_dir.join(MAN_PAGE))?.write_all(&page)?;
    Ok(())
}
