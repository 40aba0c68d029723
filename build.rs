// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

/* With the static-link feature the cryptoki module is linked into the
 * final binary instead of being loaded at runtime. The library to link
 * is named by CKBIND_STATIC_LIB (without the lib prefix or extension)
 * and searched in CKBIND_STATIC_LIB_DIR when set. */

fn main() {
    println!("cargo:rerun-if-env-changed=CKBIND_STATIC_LIB");
    println!("cargo:rerun-if-env-changed=CKBIND_STATIC_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_STATIC_LINK").is_none() {
        return;
    }

    let lib = match std::env::var("CKBIND_STATIC_LIB") {
        Ok(l) => l,
        Err(_) => {
            println!(
                "cargo:warning=static-link enabled but CKBIND_STATIC_LIB \
                 is not set, the C_* symbols must be provided by the \
                 final link"
            );
            return;
        }
    };
    if let Ok(dir) = std::env::var("CKBIND_STATIC_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rustc-link-lib={lib}");
}
