use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use memocache::{Func, MemoError};
use memocache_test::HitCounter;
use reqwest::Url;

use crate::{DUPLICATE_SUPPRESSING, build};

fn http_get_body() -> Func<Url, String, reqwest::Error> {
    let client = reqwest::Client::new();
    Arc::new(move |url| {
        let client = client.clone();
        async move {
            let response = client.get(url).send().await?.error_for_status()?;
            response.text().await
        }
        .boxed()
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_url_is_fetched_once() {
    memocache_test::setup();

    let server = HitCounter::new();

    for name in DUPLICATE_SUPPRESSING {
        let memo = build(name, http_get_body());
        let urls = [
            server.url("delay/100ms/first"),
            server.url("delay/50ms/second"),
            server.url("third"),
        ];

        let requests = urls
            .iter()
            .cycle()
            .take(urls.len() * 10)
            .map(|url| memo.get(url.clone()));
        let bodies: Vec<_> = join_all(requests)
            .await
            .into_iter()
            .map(|body| body.unwrap())
            .collect();

        assert_eq!(bodies[0].as_str(), "first", "{name}");
        assert_eq!(bodies[1].as_str(), "second", "{name}");
        assert_eq!(bodies[2].as_str(), "third", "{name}");

        assert_eq!(
            server.all_hits(),
            [
                ("/delay/100ms/first".to_owned(), 1),
                ("/delay/50ms/second".to_owned(), 1),
                ("/third".to_owned(), 1),
            ],
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_failed_fetch_is_not_retried() {
    memocache_test::setup();

    let server = HitCounter::new();
    let memo = build("memo", http_get_body());
    let url = server.url("fail/missing");

    for _ in 0..3 {
        let err = memo.get(url.clone()).await.unwrap_err();
        let MemoError::Failed(err) = err else {
            panic!("expected a failed request, got {err:?}");
        };
        assert_eq!(
            err.status(),
            Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    assert_eq!(server.accesses(), 1);
}
