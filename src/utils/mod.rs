pub mod id_generator;
pub mod json_ext;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
