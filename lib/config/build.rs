use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::PathBuf};

/// Layout of `flags.json`: a `default` table, optionally overridden per target architecture.
#[derive(Deserialize)]
struct FlagFile {
    default: BTreeMap<String, String>,
    #[serde(default)]
    arch: BTreeMap<String, BTreeMap<String, String>>,
}

fn parse_value(key: &str, raw: &str) -> usize {
    let clean = raw.trim().replace('_', "");
    let parsed = match clean.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => clean.parse::<usize>(),
    };
    parsed.unwrap_or_else(|err| panic!("Invalid value '{}' for flag '{}': {}", raw, key, err))
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let flags_path = PathBuf::from(manifest_dir).join("../../flags.json");
    let flags_str = fs::read_to_string(&flags_path).unwrap();
    let file: FlagFile = serde_json::from_str(&flags_str).unwrap();

    let mut flags = file.default;
    if let Some(overrides) = file.arch.get(target_arch.as_str()) {
        for (key, value) in overrides {
            flags.insert(key.clone(), value.clone());
        }
    }
    make_flags(&flags);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../flags.json");
}

fn make_flags(flags: &BTreeMap<String, String>) {
    let mut s = String::new();
    for (key, raw) in flags {
        let value = parse_value(key, raw);
        s += format!("/// `{}` from flags.json.\n", key).as_str();
        s += format!("pub const {}: usize = {:#x};\n", key, value).as_str();
    }
    let out_dir = env::var("OUT_DIR").unwrap();
    let path = PathBuf::from(out_dir).join("build_flags.rs");
    fs::write(path, s).unwrap();
}
