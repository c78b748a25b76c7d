pub mod export;
pub mod parquet;

#[must_use]
pub fn adapter_name() -> &'static str {
    "parqview-adapters"
}

#[cfg(test)]
mod tests {
    use super::adapter_name;

    #[test]
    fn adapter_name_is_stable() {
        assert_eq!(adapter_name(), "parqview-adapters");
    }
}
