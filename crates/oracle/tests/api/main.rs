mod refresh_cycle;
