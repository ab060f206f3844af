pub mod test_util;
