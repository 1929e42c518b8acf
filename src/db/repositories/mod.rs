mod time_entries;
