#[cfg(test)]
pub mod test_server;
pub mod url;
