// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=ANDROID_VERSION_MAJOR");

    if std::env::var_os("CARGO_FEATURE_GBINDER").is_some() {
        // The binder backend links against the system libgbinder and its glib main loop.
        pkg_config::Config::new().probe("libgbinder").unwrap();
        pkg_config::Config::new().probe("glib-2.0").unwrap();
    }
}
