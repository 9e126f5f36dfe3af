pub mod manifest_utils;
