//! # Dexdata
//!
//! A library for reading, editing and writing the class data of Android dex files: field and
//! method definitions, static values, annotations directories, code items and hidden api flags.
//!
//! ```no_run
//!  use dexdata::dex::{DexClasses, DexOptions};
//!  use dexdata::types::MethodKey;
//!
//!  let bytes = std::fs::read("classes.dex").unwrap();
//!  let mut classes = DexClasses::read(&bytes, DexOptions::default()).unwrap();
//!  for class in classes.iter() {
//!      println!("{}: {:?}", class.class_type(), class.class_data().map(|d| d.counts()));
//!  }
//!  let (out, _layout) = classes.write().unwrap();
//!  std::fs::write("classes-out.dex", out).unwrap();
//! ```

pub mod dex;
#[cfg(test)]
mod tests;
pub mod types;
