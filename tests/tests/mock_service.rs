mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    #[ntest::timeout(20_000)]
    fn outlives_the_first_test_runtime() {
        let first = runtime();
        first.block_on(init());
        assert!(first.block_on(mock_alive()));
        drop(first);

        let second = runtime();
        second.block_on(init());
        assert!(second.block_on(mock_alive()));
    }
}
