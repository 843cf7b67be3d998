//! Binary entrypoint for the calculator plugin.

use std::io::{self, Write};

use tether_plugin_calculator::run;

fn main() {
    if let Err(error) = run() {
        writeln!(io::stderr().lock(), "{error}").ok();
        std::process::exit(1);
    }
}
