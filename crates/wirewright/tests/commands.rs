use clap::Parser;
use tempfile::TempDir;

use wirewright::cli::Cli;
use wirewright::commands::{self, Report};
use wirewright::config::{ConfigToml, Settings};
use wirewright::db::{RecordStore, StoreError};
use wirewright::error::AppError;
use wirewright::output::OutputFormat;
use wirewright::write_report;

// -- Helpers --

struct Harness {
    dir: TempDir,
    settings: Settings,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_parts(dir.path().join("db.sqlite3"), &ConfigToml::default());
        Self { dir, settings }
    }

    /// Run one command the way `run` does: commit on success, roll back on error.
    async fn run(&self, args: &[&str]) -> Result<Report, AppError> {
        let cli = Cli::try_parse_from(std::iter::once("wirewright").chain(args.iter().copied())).unwrap();
        let mut store = RecordStore::open(&self.settings.db_path, self.settings.busy_timeout).await?;
        match commands::execute(&mut store, cli.command, &self.settings).await {
            Ok(report) => {
                store.commit().await?;
                Ok(report)
            }
            Err(err) => {
                store.rollback().await?;
                Err(err)
            }
        }
    }

    async fn add_wg0(&self) {
        self.run(&[
            "interface",
            "add",
            "wg0",
            "--endpoint",
            "vpn.example.com:51820",
            "--ipv4",
            "10.0.0.1/30",
            "--ipv6",
            "fd00::1/64",
        ])
        .await
        .unwrap();
    }
}

fn printed(report: &Report, format: OutputFormat) -> String {
    let mut out = Vec::new();
    write_report(&mut out, report, format).unwrap();
    String::from_utf8(out).unwrap()
}

// -- Tests --

#[tokio::test]
async fn client_add_prints_config() {
    let h = Harness::new();
    h.add_wg0().await;

    let report = h.run(&["client", "add", "wg0", "phone", "--preshared-key"]).await.unwrap();
    let text = printed(&report, OutputFormat::Table);
    assert!(text.starts_with("[Interface]\nAddress = 10.0.0.2, fd00::2\n"));
    assert!(text.contains("DNS = 1.1.1.1,8.8.8.8\n"));
    assert!(text.contains("AllowedIPs = 0.0.0.0/0, 64:ff9b::/96, 2000::/3\n"));
    assert!(text.contains("Endpoint = vpn.example.com:51820\n"));
    assert!(text.contains("[Peer]\nPresharedKey = "));
}

#[tokio::test]
async fn client_add_qr_prints_only_code() {
    let h = Harness::new();
    h.add_wg0().await;

    let report = h.run(&["client", "add", "wg0", "phone", "--qr"]).await.unwrap();
    let text = printed(&report, OutputFormat::Table);
    assert!(!text.contains("[Interface]"));
    assert!(text.lines().count() > 10);
}

#[tokio::test]
async fn concrete_pool_scenario() {
    let h = Harness::new();
    h.add_wg0().await;
    h.run(&["client", "add", "wg0", "c1"]).await.unwrap();
    h.run(&["client", "add", "wg0", "c2"]).await.unwrap();

    let err = h.run(&["client", "add", "wg0", "c3"]).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("exhausted"));

    let Report::Clients(rows) = h.run(&["client", "list"]).await.unwrap() else {
        panic!("expected client rows");
    };
    let ipv4: Vec<_> = rows.iter().map(|r| r.ipv4.clone().unwrap()).collect();
    assert_eq!(ipv4, ["10.0.0.2", "10.0.0.3"]);
}

#[tokio::test]
async fn readd_replaces_but_keeps_created_at() {
    let h = Harness::new();
    h.add_wg0().await;
    h.run(&["client", "add", "wg0", "c1"]).await.unwrap();

    let mut store = RecordStore::open(&h.settings.db_path, h.settings.busy_timeout).await.unwrap();
    let before = store.load_interface("wg0").await.unwrap();
    store.rollback().await.unwrap();

    h.run(&[
        "interface",
        "add",
        "wg0",
        "--endpoint",
        "other.example.com:1",
        "--ipv4",
        "10.9.0.1/24",
        "--listen-port",
        "0",
    ])
    .await
    .unwrap();

    let mut store = RecordStore::open(&h.settings.db_path, h.settings.busy_timeout).await.unwrap();
    let after = store.load_interface("wg0").await.unwrap();
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.address_shift, 1);
    assert_eq!(after.ipv6, None);
    assert_ne!(after.private_key, before.private_key);
    assert!((1024..=65000).contains(&after.listen_port));
    assert_eq!(store.list_clients("wg0").await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_keeps_keys_and_shift() {
    let h = Harness::new();
    h.add_wg0().await;
    h.run(&["client", "add", "wg0", "c1"]).await.unwrap();

    let report = h
        .run(&["interface", "update", "wg0", "--mtu", "1280", "--no-ipv6", "--dns", "9.9.9.9"])
        .await
        .unwrap();
    let Report::Interfaces(rows) = report else {
        panic!("expected interface rows");
    };
    assert_eq!(rows[0].mtu, 1280);
    assert_eq!(rows[0].ipv6, None);
    assert_eq!(rows[0].dns, ["9.9.9.9"]);
    assert_eq!(rows[0].address_shift, 2);
    assert_eq!(rows[0].endpoint, "vpn.example.com:51820");
}

#[tokio::test]
async fn failed_update_is_rolled_back() {
    let h = Harness::new();
    h.add_wg0().await;

    let err = h
        .run(&["interface", "update", "wg0", "--mtu", "1280", "--ipv4", "10.0.0.1/31"])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Store(StoreError::Pool(_))));

    let Report::Interfaces(rows) = h.run(&["interface", "list"]).await.unwrap() else {
        panic!("expected interface rows");
    };
    assert_eq!(rows[0].mtu, 1420);
    assert_eq!(rows[0].ipv4.as_deref(), Some("10.0.0.1/30"));
}

#[tokio::test]
async fn remove_missing_interface_fails() {
    let h = Harness::new();
    let err = h.run(&["interface", "remove", "wg0"]).await.unwrap_err();
    assert!(matches!(err, AppError::Store(StoreError::InterfaceNotFound(_))));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn remove_missing_client_succeeds() {
    let h = Harness::new();
    h.add_wg0().await;
    h.run(&["client", "add", "wg0", "c1"]).await.unwrap();

    let report = h.run(&["client", "remove", "wg0", "ghost", "c1"]).await.unwrap();
    assert!(matches!(report, Report::Done));

    let Report::Clients(rows) = h.run(&["client", "list", "--interface", "wg0"]).await.unwrap() else {
        panic!("expected client rows");
    };
    assert!(rows.is_empty());
}

#[tokio::test]
async fn render_uses_output_dir() {
    let h = Harness::new();
    h.add_wg0().await;
    let out = h.dir.path().join("etc");
    let out_arg = out.to_str().unwrap();

    let Report::Rendered(paths) = h.run(&["render", "systemd", "-o", out_arg]).await.unwrap() else {
        panic!("expected rendered paths");
    };
    assert_eq!(paths, [out.join("wg0.netdev"), out.join("wg0.network")]);
}

#[tokio::test]
async fn interface_list_as_csv() {
    let h = Harness::new();
    h.add_wg0().await;

    let report = h.run(&["interface", "list"]).await.unwrap();
    let csv = printed(&report, OutputFormat::Csv);
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("interface,endpoint,public_key,ipv4,ipv6,mtu,listen_port,dns,allowed_ips,address_shift")
    );
    let row = lines.next().unwrap();
    assert!(row.starts_with("wg0,vpn.example.com:51820,"));
    assert!(row.ends_with(",10.0.0.1/30,fd00::1/64,1420,51820,\"1.1.1.1,8.8.8.8\",\"0.0.0.0/0,64:ff9b::/96,2000::/3\",1"));
}

#[tokio::test]
async fn client_add_refuses_unusable_server_key() {
    let h = Harness::new();
    h.add_wg0().await;

    let mut store = RecordStore::open(&h.settings.db_path, h.settings.busy_timeout).await.unwrap();
    let mut wg0 = store.load_interface("wg0").await.unwrap();
    wg0.public_key = "not-a-key".to_string();
    store.save_interface(&wg0).await.unwrap();
    store.commit().await.unwrap();

    let err = h.run(&["client", "add", "wg0", "phone"]).await.unwrap_err();
    assert!(
        matches!(err, AppError::Store(StoreError::Corrupt { column: "interfaces.public_key", .. })),
        "unexpected error {err:?}"
    );

    let Report::Clients(rows) = h.run(&["client", "list"]).await.unwrap() else {
        panic!("expected client rows");
    };
    assert!(rows.is_empty());
}
