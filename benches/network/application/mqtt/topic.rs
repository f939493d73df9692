use criterion::Criterion;
use libiot_connect::network::application::mqtt::topic;

const FILTERS: [&str; 6] = [
    "devices/+/telemetry",
    "devices/sensor-7/#",
    "devices/+/commands/+",
    "fleet/#",
    "#",
    "devices/sensor-7/commands/reboot",
];

const TOPICS: [&str; 4] = [
    "devices/sensor-7/telemetry",
    "devices/sensor-7/commands/reboot",
    "fleet/eu/west/gateway-3/status",
    "$SYS/broker/uptime",
];

pub fn bench_filter_matching(c: &mut Criterion) {
    c.bench_function("topic_matches", |b| {
        b.iter(|| {
            let mut hits = 0;
            for filter in FILTERS {
                for name in TOPICS {
                    if topic::matches(filter, name) {
                        hits += 1;
                    }
                }
            }
            hits
        })
    });
}
