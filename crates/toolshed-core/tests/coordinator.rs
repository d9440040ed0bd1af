//! Integration tests for the coordinator module.

mod common;

use std::time::Duration;

use common::{FakeDownloader, Harness, release_package, release_url, tar_gz};
use tokio_util::sync::CancellationToken;
use toolshed_core::checksum::ChecksumLedger;
use toolshed_core::shim::shim_path;
use toolshed_core::{BatchOptions, EngineError};
use toolshed_schema::{PackageInfo, SourceKind};

fn archive(name: &str) -> Vec<u8> {
    let path = format!("bin/{name}");
    tar_gz(&[(path.as_str(), format!("#!/bin/sh\necho {name}\n").as_bytes())])
}

/// An `http` package whose versions come from the registry itself.
fn listed_package(versions: &[&str]) -> PackageInfo {
    let mut info = release_package("listed");
    info.source = SourceKind::Http;
    info.repo = None;
    info.asset = None;
    info.url = Some(
        "https://downloads.example.com/listed/{{.Version}}/listed_{{.OS}}_{{.Arch}}.tar.gz".into(),
    );
    info.versions = versions.iter().map(ToString::to_string).collect();
    info
}

#[tokio::test]
async fn concurrent_requests_for_one_artifact_download_once() {
    let downloader = FakeDownloader::with_delay(Duration::from_millis(50));
    let url = release_url("tool", "v1.0.0");
    downloader.serve(&url, archive("tool"));
    let h = Harness::with_config(downloader, |c| c.max_parallelism = 8);
    let coordinator = h.coordinator(ChecksumLedger::new());
    let info = release_package("tool");

    let requests = (0..8).map(|_| h.request(&info, "v1.0.0")).collect();
    let outcomes = coordinator
        .install_all(requests, &BatchOptions::default())
        .await;

    assert_eq!(outcomes.len(), 8);
    assert_eq!(h.downloader.fetches(&url), 1);
    let first = outcomes[0].result.as_ref().unwrap();
    for outcome in &outcomes {
        assert_eq!(outcome.result.as_ref().unwrap(), first);
    }
    assert!(h.bin("tool").exists());
}

#[tokio::test]
async fn separate_coordinators_share_the_store() {
    let downloader = FakeDownloader::default();
    let url = release_url("tool", "v1.0.0");
    downloader.serve(&url, archive("tool"));
    let h = Harness::new(downloader);
    let info = release_package("tool");

    for _ in 0..2 {
        let outcomes = h
            .coordinator(ChecksumLedger::new())
            .install_all(vec![h.request(&info, "v1.0.0")], &BatchOptions::default())
            .await;
        assert!(outcomes[0].is_ok());
    }
    assert_eq!(h.downloader.fetches(&url), 1);
}

#[tokio::test]
async fn one_failure_does_not_fail_siblings() {
    let downloader = FakeDownloader::default();
    downloader.serve(&release_url("good", "v1.0.0"), archive("good"));
    let h = Harness::new(downloader);
    let coordinator = h.coordinator(ChecksumLedger::new());

    let mut unsupported = release_package("never");
    unsupported.supported_envs = vec!["windows".into()];
    let requests = vec![
        h.request(&release_package("missing"), "v1.0.0"),
        h.request(&release_package("good"), "v1.0.0"),
        h.request(&unsupported, "v1.0.0"),
    ];

    let outcomes = coordinator
        .install_all(requests, &BatchOptions::default())
        .await;
    assert!(matches!(
        outcomes[0].result,
        Err(EngineError::DownloadFailed { .. })
    ));
    assert!(outcomes[1].is_ok());
    assert!(matches!(
        outcomes[2].result,
        Err(EngineError::UnsupportedPlatform { .. })
    ));
    assert_eq!(outcomes[1].package.name.as_str(), "acme/good");
}

#[tokio::test]
async fn all_or_nothing_cancels_the_rest() {
    let downloader = FakeDownloader::default();
    let slow = release_url("slow", "v1.0.0");
    let _parked = downloader.gate(&slow);
    let h = Harness::with_config(downloader, |c| c.max_parallelism = 2);
    let coordinator = h.coordinator(ChecksumLedger::new());

    let mut broken = release_package("broken");
    broken.format = Some("rar".into());
    let requests = vec![
        h.request(&release_package("slow"), "v1.0.0"),
        h.request(&broken, "v1.0.0"),
    ];

    let options = BatchOptions {
        all_or_nothing: true,
        cancel: CancellationToken::new(),
    };
    let outcomes = coordinator.install_all(requests, &options).await;

    assert!(matches!(outcomes[0].result, Err(EngineError::Cancelled)));
    assert!(matches!(
        outcomes[1].result,
        Err(EngineError::UnsupportedArchive { .. })
    ));
    // The caller's token is untouched; only the batch was cancelled.
    assert!(!options.cancel.is_cancelled());
}

#[tokio::test]
async fn cancellation_stops_unstarted_installs_and_keeps_published_ones() {
    let downloader = FakeDownloader::default();
    downloader.serve(&release_url("first", "v1.0.0"), archive("first"));
    let slow = release_url("second", "v1.0.0");
    let started = downloader.gate(&slow);
    downloader.serve(&release_url("third", "v1.0.0"), archive("third"));
    let h = Harness::with_config(downloader, |c| c.max_parallelism = 1);
    let coordinator = h.coordinator(ChecksumLedger::new());

    let requests = vec![
        h.request(&release_package("first"), "v1.0.0"),
        h.request(&release_package("second"), "v1.0.0"),
        h.request(&release_package("third"), "v1.0.0"),
    ];
    let options = BatchOptions::default();
    let cancel = options.cancel.clone();

    let batch = coordinator.install_all(requests, &options);
    let canceller = async move {
        started.notified().await;
        cancel.cancel();
    };
    let (outcomes, ()) = tokio::join!(batch, canceller);

    let entry = outcomes[0].result.as_ref().unwrap();
    assert!(matches!(outcomes[1].result, Err(EngineError::Cancelled)));
    assert!(matches!(outcomes[2].result, Err(EngineError::Cancelled)));
    assert_eq!(h.downloader.fetches(&release_url("third", "v1.0.0")), 0);

    // The entry published before cancellation is still complete.
    let store = coordinator.installer().store();
    assert_eq!(store.lookup(&entry.key).as_ref(), Some(entry));
    assert!(h.bin("first").exists());
}

#[tokio::test]
async fn batch_deadline_cancels_cooperatively() {
    let downloader = FakeDownloader::default();
    let slow = release_url("slow", "v1.0.0");
    let _parked = downloader.gate(&slow);
    let h = Harness::with_config(downloader, |c| {
        c.batch_timeout = Some(Duration::from_millis(100));
    });
    let coordinator = h.coordinator(ChecksumLedger::new());

    let outcomes = coordinator
        .install_all(
            vec![h.request(&release_package("slow"), "v1.0.0")],
            &BatchOptions::default(),
        )
        .await;
    assert!(matches!(outcomes[0].result, Err(EngineError::Cancelled)));
}

#[tokio::test]
async fn latest_skips_prereleases() {
    let info = listed_package(&["1.0.0", "1.1.0", "2.0.0-rc1"]);
    let url = "https://downloads.example.com/listed/1.1.0/listed_linux_amd64.tar.gz";
    let downloader = FakeDownloader::default();
    downloader.serve(url, archive("listed"));
    let h = Harness::new(downloader);

    let outcomes = h
        .coordinator(ChecksumLedger::new())
        .install_all(vec![h.request(&info, "latest")], &BatchOptions::default())
        .await;
    let outcome = &outcomes[0];
    let entry = outcome.result.as_ref().unwrap();
    assert_eq!(entry.key.version.as_str(), "1.1.0");
    assert_eq!(
        outcome.package.resolved.as_ref().map(|v| v.as_str()),
        Some("1.1.0")
    );
    assert_eq!(h.downloader.fetches(url), 1);
}

#[tokio::test]
async fn range_requests_pick_newest_inside_range() {
    let info = listed_package(&["1.0.0", "1.4.2", "2.0.0"]);
    let url = "https://downloads.example.com/listed/1.4.2/listed_linux_amd64.tar.gz";
    let downloader = FakeDownloader::default();
    downloader.serve(url, archive("listed"));
    let h = Harness::new(downloader);

    let entry = h
        .coordinator(ChecksumLedger::new())
        .ensure_installed(h.request(&info, "^1"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(entry.key.version.as_str(), "1.4.2");
}

#[tokio::test]
async fn no_matching_version_is_reported() {
    let info = listed_package(&["2.0.0-rc1"]);
    let h = Harness::new(FakeDownloader::default());

    let outcomes = h
        .coordinator(ChecksumLedger::new())
        .install_all(vec![h.request(&info, "latest")], &BatchOptions::default())
        .await;
    assert!(matches!(
        outcomes[0].result,
        Err(EngineError::NoVersionFound { .. })
    ));
    assert_eq!(h.downloader.total(), 0);
}

#[tokio::test]
async fn lazy_shims_defer_installation() {
    let h = Harness::new(FakeDownloader::default());
    let coordinator = h.coordinator(ChecksumLedger::new());
    let requests = vec![h.request(&release_package("tool"), "v1.0.0")];

    let linked = coordinator
        .link_lazy(&requests, &h.root().join("toolshed"))
        .unwrap();
    assert_eq!(linked, vec![shim_path(&h.config.bin_dir(), "tool")]);
    assert_eq!(h.downloader.total(), 0);
    assert!(coordinator.installer().store().installed().is_empty());
}

#[tokio::test]
async fn disabled_lazy_install_never_downloads() {
    let downloader = FakeDownloader::default();
    let url = release_url("tool", "v1.0.0");
    downloader.serve(&url, archive("tool"));
    let h = Harness::with_config(downloader, |c| c.disable_lazy_install = true);
    let coordinator = h.coordinator(ChecksumLedger::new());
    let info = release_package("tool");
    let cancel = CancellationToken::new();

    let err = coordinator
        .ensure_installed(h.request(&info, "v1.0.0"), &cancel)
        .await
        .unwrap_err();
    assert!(
        matches!(&err, EngineError::NotInstalled { package, version }
            if package == "standard/acme/tool" && version == "v1.0.0"),
        "{err}"
    );
    assert_eq!(h.downloader.total(), 0);
    assert!(coordinator.installer().store().installed().is_empty());

    // An explicit install still works, after which exec finds the entry.
    let outcomes = coordinator
        .install_all(vec![h.request(&info, "v1.0.0")], &BatchOptions::default())
        .await;
    assert!(outcomes[0].is_ok());
    let entry = coordinator
        .ensure_installed(h.request(&info, "v1.0.0"), &cancel)
        .await
        .unwrap();
    assert!(entry.command_path("tool").unwrap().is_file());
    assert_eq!(h.downloader.fetches(&url), 1);
}
