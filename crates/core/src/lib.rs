pub mod audit_trail;
pub mod edits;
pub mod executor;
pub mod normalizer;
pub mod pager;
pub mod save_guard;
pub mod session;
pub mod settings;
pub mod sort;
pub mod sql_text;

#[cfg(test)]
pub(crate) mod test_support;

#[must_use]
pub fn domain_name() -> &'static str {
    "parqview-core"
}

#[cfg(test)]
mod tests {
    use super::domain_name;

    #[test]
    fn domain_name_is_stable() {
        assert_eq!(domain_name(), "parqview-core");
    }
}
