use std::collections::HashMap;
use std::fmt::Write;
use std::path::PathBuf;
use std::{env, fs};

static CONFIGS: &[(&str, usize)] = &[
    // name, default
    ("EVENT_OVERHEAD_START_US", 300),
    ("PDU_POOL_SIZE", 6),
];

const PREFIX: &str = "TROUBLE_CONTROLLER_";

fn main() {
    let mut configs = HashMap::new();
    for (name, default) in CONFIGS {
        configs.insert(name.to_string(), *default);
    }

    for (var, value) in env::vars() {
        if let Some(name) = var.strip_prefix(PREFIX) {
            match configs.get_mut(name) {
                Some(v) => {
                    *v = value
                        .parse()
                        .unwrap_or_else(|_| panic!("{} must be an unsigned integer, got {:?}", var, value));
                }
                None => panic!("Unknown configuration {}", var),
            }
        }
    }

    let mut data = String::new();
    for (name, value) in CONFIGS.iter().map(|(name, _)| (name, configs[*name])) {
        writeln!(&mut data, "pub const {}: usize = {};", name, value).unwrap();
    }

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    fs::write(out_dir.join("config.rs"), data).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
    for (name, _) in CONFIGS {
        println!("cargo:rerun-if-env-changed={}{}", PREFIX, name);
    }
}
