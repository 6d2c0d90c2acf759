use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    let Ok(crate_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let crate_dir = PathBuf::from(crate_dir);
    let config = cbindgen::Config::from_file(crate_dir.join("cbindgen.toml")).unwrap_or_default();

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            let include = crate_dir.join("include");
            if std::fs::create_dir_all(&include).is_ok() {
                bindings.write_to_file(include.join("coach_runtime.h"));
            }
        }
        // A header is a convenience for the host build; never fail the crate over it.
        Err(e) => println!("cargo:warning=could not generate C header: {e}"),
    }
}
