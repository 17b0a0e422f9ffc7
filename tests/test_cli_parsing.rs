// Focused CLI parsing tests (tests command-line parsing only, not business logic)

use clap::Parser;
use std::path::PathBuf;
use vmrun::cli::Cli;
use vmrun::firecracker::OutputMode;

#[test]
fn test_all_flag_forms_parse() {
    let test_cases = vec![
        vec!["vmrun"],
        vec!["vmrun", "--print-config"],
        vec!["vmrun", "--config", "/etc/vmrun.json"],
        vec!["vmrun", "--kernel", "/k", "--initrd", "/i", "--rootfs", "/r"],
        vec!["vmrun", "--rootfs-writable", "--root-device"],
        vec!["vmrun", "--guest-cid", "5", "--vsock-port", "1024"],
        vec!["vmrun", "--env", "A=1", "--env", "B=2"],
        vec!["vmrun", "--strict-readiness", "--log-firecracker"],
        vec!["vmrun", "--", "/bin/sh", "-c", "echo hi"],
    ];

    for args in test_cases {
        Cli::try_parse_from(&args).unwrap_or_else(|e| panic!("Failed to parse {:?}: {}", args, e));
    }
}

#[test]
fn test_all_overrides_applied() {
    let cli = Cli::try_parse_from([
        "vmrun",
        "--firecracker",
        "/opt/fc/firecracker",
        "--kernel",
        "/images/vmlinux",
        "--initrd",
        "/images/init.cpio",
        "--boot-args",
        "console=ttyS0",
        "--rootfs",
        "/images/root.ext4",
        "--rootfs-writable",
        "--root-device",
        "--guest-cid",
        "7",
        "--vsock-port",
        "52",
        "--env",
        "FOO=bar",
        "--strict-readiness",
        "--log-firecracker",
        "--",
        "/sbin/init",
        "--verbose",
    ])
    .unwrap();

    let config = cli.resolve_config().unwrap();
    assert_eq!(config.firecracker_bin, PathBuf::from("/opt/fc/firecracker"));
    assert_eq!(
        config.boot_source.kernel_image_path,
        PathBuf::from("/images/vmlinux")
    );
    assert_eq!(
        config.boot_source.initrd_path,
        Some(PathBuf::from("/images/init.cpio"))
    );
    assert_eq!(config.boot_source.boot_args, "console=ttyS0");
    assert_eq!(config.drive.path_on_host, PathBuf::from("/images/root.ext4"));
    assert!(!config.drive.is_read_only);
    assert!(config.drive.is_root_device);
    assert_eq!(config.side_channel.guest_cid, 7);
    assert_eq!(config.side_channel.port, 52);
    assert_eq!(config.guest.envp, vec!["FOO=bar"]);
    // Flags after `--` belong to the guest command, not to us
    assert_eq!(config.guest.argv, vec!["/sbin/init", "--verbose"]);
    assert!(config.readiness.fail_on_timeout);
    assert_eq!(config.hypervisor_output, OutputMode::Log);
}

#[test]
fn test_env_replaces_default_environment() {
    let cli = Cli::try_parse_from(["vmrun", "--env", "ONLY=this"]).unwrap();
    let config = cli.resolve_config().unwrap();
    assert_eq!(config.guest.envp, vec!["ONLY=this"]);
    // argv untouched without `--`
    assert_eq!(config.guest.argv[0], "/usr/local/bin/docker-entrypoint.sh");
}

#[test]
fn test_invalid_values_rejected() {
    assert!(Cli::try_parse_from(["vmrun", "--guest-cid", "three"]).is_err());
    assert!(Cli::try_parse_from(["vmrun", "--vsock-port", "-1"]).is_err());
    assert!(Cli::try_parse_from(["vmrun", "--no-such-flag"]).is_err());
}

#[test]
fn test_missing_config_file_is_error() {
    let cli = Cli::try_parse_from(["vmrun", "--config", "/nonexistent/vmrun.json"]).unwrap();
    let err = cli.resolve_config().unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/vmrun.json"));
}

#[test]
fn test_bad_env_fails_validation() {
    let cli = Cli::try_parse_from(["vmrun", "--env", "NOEQUALS"]).unwrap();
    let config = cli.resolve_config().unwrap();
    assert!(config.validate().is_err());
}
