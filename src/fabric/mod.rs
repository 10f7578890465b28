//! Message fabric (spec §4.3, C3): AMQP 0.9.1 topic exchanges, durable
//! queues with TTL/max-length/DLQ policy, manual-ack consumers with
//! per-queue-family prefetch.
//!
//! The teacher talks to exchanges directly over REST/websocket and has no
//! broker of its own; this module is new, grounded on the shape of
//! `scrapers::binance_session` (a pooled, reconnecting client wrapped in a
//! small typed handle) but built against `lapin`/`deadpool-lapin` per
//! `SPEC_FULL.md` §10.2.

pub mod topology;

use crate::error::MasterTradeError;
use crate::models::RawMessage;
use deadpool_lapin::{Manager, Pool, Runtime};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, ExchangeKind};
use topology::{Overflow, DLQ_TTL_SECS, DLX_EXCHANGE, EXCHANGES, QUEUES};

#[derive(Clone)]
pub struct Fabric {
    pool: Pool,
}

impl Fabric {
    pub async fn connect(amqp_url: &str) -> Result<Self, MasterTradeError> {
        let manager = Manager::new(amqp_url.to_string(), lapin::ConnectionProperties::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "build amqp pool".into(),
                source: anyhow::anyhow!(e.to_string()),
            })?;

        let fabric = Self { pool };
        fabric.declare_topology().await?;
        Ok(fabric)
    }

    async fn channel(&self) -> Result<Channel, MasterTradeError> {
        let conn = self.pool.get().await.map_err(|e| MasterTradeError::InfrastructureStore {
            what: "amqp pool checkout".into(),
            source: anyhow::anyhow!(e.to_string()),
        })?;
        conn.create_channel()
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "amqp create_channel".into(),
                source: e.into(),
            })
    }

    /// Idempotent: declares every exchange, the DLX, and every queue with
    /// its TTL/max-length/overflow/dead-letter arguments, then binds it.
    pub async fn declare_topology(&self) -> Result<(), MasterTradeError> {
        let channel = self.channel().await?;

        for ex in EXCHANGES {
            channel
                .exchange_declare(
                    ex.name,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        auto_delete: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MasterTradeError::InfrastructureStore {
                    what: format!("declare exchange {}", ex.name),
                    source: e.into(),
                })?;
        }

        for q in QUEUES {
            let mut args = FieldTable::default();
            args.insert(
                ShortString::from("x-message-ttl"),
                AMQPValue::LongUInt((q.ttl_secs * 1000) as u32),
            );
            args.insert(
                ShortString::from("x-max-length"),
                AMQPValue::LongUInt(q.max_length),
            );
            if matches!(q.overflow, Overflow::DropHead) {
                args.insert(
                    ShortString::from("x-overflow"),
                    AMQPValue::LongString(LongString::from("drop-head")),
                );
            }
            if q.dlq_routed {
                args.insert(
                    ShortString::from("x-dead-letter-exchange"),
                    AMQPValue::LongString(LongString::from(DLX_EXCHANGE)),
                );
                args.insert(
                    ShortString::from("x-dead-letter-routing-key"),
                    AMQPValue::LongString(LongString::from(topology::dlq_routing_key(q.name))),
                );
            }

            channel
                .queue_declare(
                    q.name,
                    QueueDeclareOptions {
                        durable: true,
                        auto_delete: false,
                        ..Default::default()
                    },
                    args,
                )
                .await
                .map_err(|e| MasterTradeError::InfrastructureStore {
                    what: format!("declare queue {}", q.name),
                    source: e.into(),
                })?;

            channel
                .queue_bind(
                    q.name,
                    q.exchange,
                    q.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MasterTradeError::InfrastructureStore {
                    what: format!("bind queue {}", q.name),
                    source: e.into(),
                })?;
        }

        let mut dlq_args = FieldTable::default();
        dlq_args.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongUInt((DLQ_TTL_SECS * 1000) as u32),
        );
        for q in QUEUES.iter().filter(|q| q.dlq_routed) {
            let sink = format!("{}.dlq", q.name);
            channel
                .queue_declare(
                    &sink,
                    QueueDeclareOptions {
                        durable: true,
                        auto_delete: false,
                        ..Default::default()
                    },
                    dlq_args.clone(),
                )
                .await
                .map_err(|e| MasterTradeError::InfrastructureStore {
                    what: format!("declare dlq sink {sink}"),
                    source: e.into(),
                })?;
            channel
                .queue_bind(
                    &sink,
                    DLX_EXCHANGE,
                    &topology::dlq_routing_key(q.name),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MasterTradeError::InfrastructureStore {
                    what: format!("bind dlq sink {sink}"),
                    source: e.into(),
                })?;
        }

        Ok(())
    }

    /// Publish with `persistent=true`, per spec §4.3.
    pub async fn publish(
        &self,
        exchange: &str,
        message: &RawMessage,
    ) -> Result<(), MasterTradeError> {
        let channel = self.channel().await?;
        let body = serde_json::to_vec(message).map_err(|e| MasterTradeError::PermanentParse {
            source_name: "RawMessage".into(),
            reason: e.to_string(),
        })?;

        channel
            .basic_publish(
                exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: format!("publish to {exchange}"),
                source: e.into(),
            })?
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: format!("publish confirm on {exchange}"),
                source: e.into(),
            })?;
        Ok(())
    }

    /// Passive declare to read `message_count` without mutating the queue,
    /// used by the signal aggregator's backpressure check (spec §5).
    pub async fn queue_depth(&self, queue: &str) -> Result<u32, MasterTradeError> {
        let channel = self.channel().await?;
        let declared = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: format!("passive declare {queue}"),
                source: e.into(),
            })?;
        Ok(declared.message_count())
    }

    pub async fn consumer(&self, queue: &str, tag: &str) -> Result<Consumer, MasterTradeError> {
        let channel = self.channel().await?;
        let prefetch = topology::prefetch_for(queue);
        channel
            .basic_qos(prefetch, lapin::options::BasicQosOptions::default())
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: format!("set qos on {queue}"),
                source: e.into(),
            })?;
        Ok(Consumer {
            channel,
            queue: queue.to_string(),
            tag: tag.to_string(),
        })
    }

    /// An exclusive, auto-delete queue bound to `mastertrade.market` with
    /// `routing_key`, torn down automatically when the owning connection
    /// (the websocket push in the Control API) disconnects. Unlike
    /// `consumer`, every caller gets its own copy of each matching
    /// message instead of competing over one durable queue.
    pub async fn ephemeral_consumer(&self, routing_key: &str) -> Result<Consumer, MasterTradeError> {
        let channel = self.channel().await?;
        let declared = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "declare ephemeral queue".into(),
                source: e.into(),
            })?;
        let queue_name = declared.name().to_string();

        channel
            .queue_bind(
                &queue_name,
                "mastertrade.market",
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: format!("bind ephemeral queue to {routing_key}"),
                source: e.into(),
            })?;

        Ok(Consumer {
            channel,
            queue: queue_name.clone(),
            tag: format!("ws-{queue_name}"),
        })
    }
}

/// Manual-ack consumer handle. The `delivery_tag` is whatever `lapin`
/// handed back on the `Delivery`; callers ack/reject it explicitly so a
/// crash mid-processing redelivers rather than silently drops (spec §5
/// cancellation/backpressure contract).
pub struct Consumer {
    channel: Channel,
    queue: String,
    tag: String,
}

impl Consumer {
    pub async fn stream(
        &self,
    ) -> Result<lapin::Consumer, MasterTradeError> {
        self.channel
            .basic_consume(
                &self.queue,
                &self.tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: format!("consume {}", self.queue),
                source: e.into(),
            })
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), MasterTradeError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "basic_ack".into(),
                source: e.into(),
            })
    }

    /// Requeue for redelivery (used on graceful shutdown and transient
    /// failures).
    pub async fn nack_requeue(&self, delivery_tag: u64) -> Result<(), MasterTradeError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "basic_nack requeue".into(),
                source: e.into(),
            })
    }

    /// Poison message: `requeue=false` routes it to the DLQ via the
    /// queue's dead-letter arguments.
    pub async fn nack_to_dlq(&self, delivery_tag: u64) -> Result<(), MasterTradeError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "basic_nack to dlq".into(),
                source: e.into(),
            })
    }
}
