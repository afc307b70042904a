use std::env;

fn main() {
    // Version reported by `htsget --version`; overridable for packaging
    let version = env::var("HTSGET_VERSION_OVERRIDE")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_default());
    println!("cargo:rustc-env=HTSGET_VERSION={version}");

    println!("cargo:rerun-if-env-changed=HTSGET_VERSION_OVERRIDE");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
